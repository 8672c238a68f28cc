//! Model registries: which models a run covers and where they come from

use serde::{Deserialize, Serialize};

/// How a registry URL turns into a deployable `.model` archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    /// `<name>.tar.gz` containing `<name>/model.onnx`; needs export
    OnnxZoo,
    /// A raw `.onnx` weight file with per-model metadata beside it; needs export
    OnnxFiles,
    /// A ready-to-serve `.model` archive
    ServerArchive,
}

impl ModelSource {
    /// Map the legacy `(is_onnx, onnx_source_model_zoo)` flag pair
    pub fn from_flags(is_onnx: bool, onnx_zoo: bool) -> Self {
        match (is_onnx, onnx_zoo) {
            (false, _) => Self::ServerArchive,
            (true, true) => Self::OnnxZoo,
            (true, false) => Self::OnnxFiles,
        }
    }

    pub fn needs_export(self) -> bool {
        !matches!(self, Self::ServerArchive)
    }

    /// Multipart field the server expects the input image under
    pub fn input_field(self) -> &'static str {
        if self.needs_export() { "input_0" } else { "data" }
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnnxZoo => write!(f, "onnx_zoo"),
            Self::OnnxFiles => write!(f, "onnx_files"),
            Self::ServerArchive => write!(f, "server_archive"),
        }
    }
}

/// Ordered, read-only mapping of model name to source URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRegistry {
    entries: Vec<(String, String)>,
}

impl ModelRegistry {
    /// Build a registry; a later duplicate name replaces the earlier URL in place
    pub fn new<I, N, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, U)>,
        N: Into<String>,
        U: Into<String>,
    {
        let mut registry = Self::default();
        for (name, url) in entries {
            let (name, url) = (name.into(), url.into());
            match registry.entries.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = url,
                None => registry.entries.push((name, url)),
            }
        }
        registry
    }

    /// Archives from the ONNX model zoo
    pub fn onnx_zoo() -> Self {
        const BASE: &str = "https://s3.amazonaws.com/download.onnx/models";
        Self::new(
            [
                "bvlc_alexnet",
                "densenet121",
                "inception_v1",
                "inception_v2",
                "resnet50",
                "shufflenet",
                "squeezenet",
                "vgg16",
                "vgg19",
            ]
            .map(|name| (name, format!("{BASE}/{name}.tar.gz"))),
        )
    }

    /// Raw ONNX weights hosted next to model-server metadata
    pub fn onnx_model_server() -> Self {
        const BASE: &str = "https://s3.amazonaws.com/model-server/models";
        Self::new([
            ("onnx-alexnet", format!("{BASE}/onnx-alexnet/alexnet.onnx")),
            ("onnx-squeezenet", format!("{BASE}/onnx-squeezenet/squeezenet.onnx")),
            ("onnx-inception_v1", format!("{BASE}/onnx-inception_v1/inception_v1.onnx")),
            ("onnx-vgg19", format!("{BASE}/onnx-vgg19/vgg19.onnx")),
        ])
    }

    /// Ready-made MXNet model-server archives
    pub fn mxnet() -> Self {
        const BASE: &str = "https://s3.amazonaws.com/model-server/models";
        Self::new([
            ("caffenet", format!("{BASE}/caffenet/caffenet.model")),
            ("Inception-BN", format!("{BASE}/inception-bn/Inception-BN.model")),
            ("nin", format!("{BASE}/nin/nin.model")),
            ("resnet-152", format!("{BASE}/resnet-152/resnet-152.model")),
            ("resnet-18", format!("{BASE}/resnet-18/resnet-18.model")),
            ("resnext-101-64x4d", format!("{BASE}/resnext-101-64x4d/resnext-101-64x4d.model")),
            ("squeezenet_v1.1", format!("{BASE}/squeezenet_v1.1/squeezenet_v1.1.model")),
            ("vgg19", format!("{BASE}/vgg19/vgg19.model")),
        ])
    }

    /// Sub-registry with only `names`, in the order given
    pub fn filtered<S: AsRef<str>>(&self, names: &[S]) -> anyhow::Result<Self> {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let url = self.url(name).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown model '{}' (known: {})",
                    name,
                    self.names().collect::<Vec<_>>().join(", ")
                )
            })?;
            entries.push((name.to_string(), url.to_string()));
        }
        Ok(Self::new(entries))
    }

    pub fn url(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, url)| url.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, url)| (name.as_str(), url.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Built-in model suites selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Suite {
    /// ONNX zoo archives, exported before serving
    OnnxZoo,
    /// Raw ONNX files with model-server metadata, exported before serving
    Onnx,
    /// Ready-made model-server archives
    Mxnet,
}

impl Suite {
    pub fn registry(self) -> ModelRegistry {
        match self {
            Self::OnnxZoo => ModelRegistry::onnx_zoo(),
            Self::Onnx => ModelRegistry::onnx_model_server(),
            Self::Mxnet => ModelRegistry::mxnet(),
        }
    }

    pub fn source(self) -> ModelSource {
        match self {
            Self::OnnxZoo => ModelSource::OnnxZoo,
            Self::Onnx => ModelSource::OnnxFiles,
            Self::Mxnet => ModelSource::ServerArchive,
        }
    }
}
