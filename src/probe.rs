//! Prediction probes against a running model server

use crate::error::ProbeError;
use serde_json::Value;
use std::path::Path;

/// `http://127.0.0.1:<port>/<model>/predict`
pub fn predict_url(port: u16, model: &str) -> String {
    format!("http://127.0.0.1:{}/{}/predict", port, model)
}

/// POST `image` as multipart field `field` and decode the JSON answer
pub async fn predict(
    client: &reqwest::Client,
    port: u16,
    model: &str,
    field: &str,
    image: &Path,
) -> Result<Value, ProbeError> {
    let bytes = tokio::fs::read(image).await.map_err(|source| ProbeError::Image {
        path: image.to_path_buf(),
        source,
    })?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());

    let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
    let form = reqwest::multipart::Form::new().part(field.to_string(), part);

    let url = predict_url(port, model);
    tracing::debug!(model = %model, url = %url, field = %field, "Sending prediction request");

    let request_error = |source: reqwest::Error| ProbeError::Request {
        model: model.to_string(),
        source,
    };

    let response = client
        .post(&url)
        .multipart(form)
        .send()
        .await
        .map_err(request_error)?;

    let status = response.status();
    let body = response.text().await.map_err(request_error)?;

    if !status.is_success() {
        return Err(ProbeError::Status {
            model: model.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|source| ProbeError::InvalidJson {
        model: model.to_string(),
        source,
    })
}

/// A prediction must be present and carry some content
pub fn assert_prediction(model: &str, prediction: &Value) -> Result<(), ProbeError> {
    let empty = match prediction {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    };

    if empty {
        return Err(ProbeError::EmptyPrediction {
            model: model.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn image_file(dir: &Path) -> std::path::PathBuf {
        let image = dir.join("kitten.jpg");
        std::fs::write(&image, b"fake-jpeg-bytes").unwrap();
        image
    }

    #[test]
    fn test_predict_url() {
        assert_eq!(predict_url(8080, "nin"), "http://127.0.0.1:8080/nin/predict");
    }

    #[test]
    fn test_assert_prediction() {
        assert!(assert_prediction("m", &json!({"prediction": [[{"class": "tabby", "probability": 0.7}]]})).is_ok());
        assert!(assert_prediction("m", &json!([0.1, 0.9])).is_ok());
        assert!(assert_prediction("m", &json!(0)).is_ok());

        for empty in [json!(null), json!([]), json!({}), json!("")] {
            assert!(
                matches!(
                    assert_prediction("m", &empty),
                    Err(ProbeError::EmptyPrediction { .. })
                ),
                "{empty} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_predict_sends_multipart_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nin/predict"))
            .and(body_string_contains("name=\"data\""))
            .and(body_string_contains("filename=\"kitten.jpg\""))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"prediction": [[{"class": "n02123045 tabby", "probability": 0.42}]]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = image_file(dir.path());
        let port = server.address().port();

        let value = predict(&reqwest::Client::new(), port, "nin", "data", &image)
            .await
            .unwrap();
        assert!(value["prediction"].is_array());
        assert!(assert_prediction("nin", &value).is_ok());
    }

    #[tokio::test]
    async fn test_predict_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = image_file(dir.path());
        let err = predict(
            &reqwest::Client::new(),
            server.address().port(),
            "vgg19",
            "input_0",
            &image,
        )
        .await
        .unwrap_err();

        match err {
            ProbeError::Status { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body, "model not loaded");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_predict_invalid_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = image_file(dir.path());
        let err = predict(&reqwest::Client::new(), server.address().port(), "nin", "data", &image)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidJson { .. }));
    }

    #[tokio::test]
    async fn test_predict_missing_image() {
        let err = predict(
            &reqwest::Client::new(),
            8080,
            "nin",
            "data",
            Path::new("/nonexistent/kitten.jpg"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProbeError::Image { .. }));
    }
}
