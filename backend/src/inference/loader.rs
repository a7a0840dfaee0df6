//! Defensive model loading.
//!
//! The serialized artifact may be a TorchScript module, a plain named-tensor
//! weights file, or a conversion from another training stack whose tensor
//! names contain characters the runtime rejects. The loader walks an ordered
//! chain of recovery strategies and stops at the first success; the final
//! strategy needs no external data, so `load_with_fallback` never fails.

use std::path::{Path, PathBuf};

use tch::nn::{self, ModuleT};
use tch::{CModule, Device, TchError, Tensor};
use tempfile::NamedTempFile;

use super::net;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("torch error: {0}")]
    Torch(#[from] TchError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact contains no tensor names requiring sanitization")]
    NothingToSanitize,
    #[error("no tensor in the artifact matched the rebuilt network")]
    NoMatchingTensors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// TorchScript artifact deserialized as-is.
    Direct,
    /// Rebuilt architecture with matching-by-name weights, mismatches skipped.
    PartialWeights,
    /// Strict load of a name-sanitized temporary copy of the artifact.
    Sanitized,
    /// Strict weights-only load, ignoring any saved training state.
    WeightsOnly,
    /// Freshly initialized minimal network; predictions are untrained.
    FallbackUntrained,
}

impl LoadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStrategy::Direct => "direct",
            LoadStrategy::PartialWeights => "partial_weights",
            LoadStrategy::Sanitized => "sanitized",
            LoadStrategy::WeightsOnly => "weights_only",
            LoadStrategy::FallbackUntrained => "fallback_untrained",
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, LoadStrategy::FallbackUntrained)
    }
}

/// A loaded network, either scripted or rebuilt in `tch::nn`. The VarStore
/// owns the rebuilt weights and must live as long as the net.
pub enum ClassifierNet {
    Scripted(CModule),
    Graph { _vs: nn::VarStore, net: nn::SequentialT },
}

impl ClassifierNet {
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, TchError> {
        tch::no_grad(|| match self {
            ClassifierNet::Scripted(module) => module.forward_ts(&[input]),
            ClassifierNet::Graph { net, .. } => Ok(net.forward_t(input, false)),
        })
    }
}

pub struct LoadedClassifier {
    pub net: ClassifierNet,
    pub strategy: LoadStrategy,
}

pub struct ModelLoader {
    artifact: PathBuf,
    device: Device,
}

impl ModelLoader {
    pub fn new(artifact: impl Into<PathBuf>, device: Device) -> Self {
        Self { artifact: artifact.into(), device }
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Walks the strategy chain. Individual failures are logged and
    /// non-fatal; the last strategy always succeeds.
    pub fn load_with_fallback(&self) -> LoadedClassifier {
        let strategies: [(LoadStrategy, fn(&Self) -> Result<ClassifierNet, LoadError>); 4] = [
            (LoadStrategy::Direct, Self::load_scripted),
            (LoadStrategy::PartialWeights, Self::load_partial_weights),
            (LoadStrategy::Sanitized, Self::load_sanitized),
            (LoadStrategy::WeightsOnly, Self::load_strict_weights),
        ];

        for (strategy, attempt) in strategies {
            match attempt(self) {
                Ok(net) => {
                    log::info!(
                        "model loaded from {} via {} strategy",
                        self.artifact.display(),
                        strategy.as_str()
                    );
                    return LoadedClassifier { net, strategy };
                }
                Err(e) => {
                    log::warn!("{} load strategy failed: {}", strategy.as_str(), e);
                }
            }
        }

        log::warn!(
            "all load strategies failed for {}; serving a freshly initialized fallback network, \
             predictions will be untrained",
            self.artifact.display()
        );
        LoadedClassifier { net: self.build_fallback(), strategy: LoadStrategy::FallbackUntrained }
    }

    fn load_scripted(&self) -> Result<ClassifierNet, LoadError> {
        let module = CModule::load_on_device(&self.artifact, self.device)?;
        Ok(ClassifierNet::Scripted(module))
    }

    fn load_partial_weights(&self) -> Result<ClassifierNet, LoadError> {
        let mut vs = nn::VarStore::new(self.device);
        let net = net::classifier(&vs.root());
        let missing = vs.load_partial(&self.artifact)?;
        // An artifact that matches nothing would leave the whole network
        // random; fail so later strategies get a chance at it.
        if missing.len() >= vs.variables().len() {
            return Err(LoadError::NoMatchingTensors);
        }
        if !missing.is_empty() {
            log::warn!(
                "{} weight tensors missing from artifact; those layers keep their random \
                 initialization",
                missing.len()
            );
        }
        Ok(ClassifierNet::Graph { _vs: vs, net })
    }

    fn load_sanitized(&self) -> Result<ClassifierNet, LoadError> {
        let sanitized = sanitize_artifact(&self.artifact)?;
        let mut vs = nn::VarStore::new(self.device);
        let net = net::classifier(&vs.root());
        vs.load(sanitized.path())?;
        Ok(ClassifierNet::Graph { _vs: vs, net })
    }

    fn load_strict_weights(&self) -> Result<ClassifierNet, LoadError> {
        let mut vs = nn::VarStore::new(self.device);
        let net = net::classifier(&vs.root());
        vs.load(&self.artifact)?;
        Ok(ClassifierNet::Graph { _vs: vs, net })
    }

    fn build_fallback(&self) -> ClassifierNet {
        let vs = nn::VarStore::new(self.device);
        let net = net::fallback_cnn(&vs.root());
        ClassifierNet::Graph { _vs: vs, net }
    }
}

/// `nn::Path` joins components with `.`, so slash-mangled names must map
/// onto the dotted form for a strict `VarStore` load to find them.
pub fn sanitize_name(name: &str) -> String {
    name.replace('/', ".")
}

/// Rewrites illegal tensor names into a temporary copy of the artifact.
/// The source file is never touched; the copy is deleted when the returned
/// handle drops, on success and failure alike.
pub fn sanitize_artifact(artifact: &Path) -> Result<NamedTempFile, LoadError> {
    let tensors = Tensor::load_multi(artifact)?;
    if !tensors.iter().any(|(name, _)| name.contains('/')) {
        return Err(LoadError::NothingToSanitize);
    }

    let renamed: Vec<(String, Tensor)> = tensors
        .into_iter()
        .map(|(name, tensor)| {
            let clean = sanitize_name(&name);
            if clean != name {
                log::debug!("sanitized tensor name: {} -> {}", name, clean);
            }
            (clean, tensor)
        })
        .collect();

    let tmp = tempfile::Builder::new().prefix("sunscan-model-").suffix(".ot").tempfile()?;
    Tensor::save_multi(&renamed, tmp.path())?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    fn write_artifact(names: &[&str]) -> NamedTempFile {
        let tensors: Vec<(String, Tensor)> = names
            .iter()
            .map(|n| (n.to_string(), Tensor::ones([2, 2], (Kind::Float, Device::Cpu))))
            .collect();
        let file = tempfile::Builder::new().suffix(".ot").tempfile().unwrap();
        Tensor::save_multi(&tensors, file.path()).unwrap();
        file
    }

    #[test]
    fn sanitize_name_rewrites_slashes_to_variable_store_form() {
        assert_eq!(sanitize_name("features/conv0/weight"), "features.conv0.weight");
        assert_eq!(sanitize_name("head.fc1.bias"), "head.fc1.bias");
    }

    #[test]
    fn sanitize_artifact_leaves_source_untouched_and_cleans_up() {
        let artifact = write_artifact(&["features/conv0/weight", "head.fc1.bias"]);
        let before = std::fs::read(artifact.path()).unwrap();

        let tmp_path;
        {
            let sanitized = sanitize_artifact(artifact.path()).unwrap();
            tmp_path = sanitized.path().to_path_buf();
            let names: Vec<String> = Tensor::load_multi(sanitized.path())
                .unwrap()
                .into_iter()
                .map(|(n, _)| n)
                .collect();
            assert!(names.contains(&"features.conv0.weight".to_string()));
            assert!(names.contains(&"head.fc1.bias".to_string()));
        }

        assert!(!tmp_path.exists(), "temporary sanitized copy must be removed");
        assert_eq!(before, std::fs::read(artifact.path()).unwrap());
    }

    #[test]
    fn sanitize_artifact_rejects_clean_files() {
        let artifact = write_artifact(&["head.fc1.weight"]);
        assert!(matches!(
            sanitize_artifact(artifact.path()),
            Err(LoadError::NothingToSanitize)
        ));
    }

    #[test]
    fn saved_weights_load_without_degradation() {
        let src_vs = nn::VarStore::new(Device::Cpu);
        let src_net = net::classifier(&src_vs.root());
        let file = tempfile::Builder::new().suffix(".ot").tempfile().unwrap();
        src_vs.save(file.path()).unwrap();

        let loader = ModelLoader::new(file.path(), Device::Cpu);
        let loaded = loader.load_with_fallback();
        assert_eq!(loaded.strategy, LoadStrategy::PartialWeights);
        assert!(!loaded.strategy.is_degraded());

        // The loaded net must compute exactly what the saved one does.
        let input = Tensor::rand([1, 3, 64, 64], (Kind::Float, Device::Cpu));
        let expected = tch::no_grad(|| src_net.forward_t(&input, false));
        let actual = loaded.net.forward(&input).unwrap();
        assert!(expected.allclose(&actual, 1e-5, 1e-8, false));
    }

    #[test]
    fn slash_named_artifact_loads_via_sanitization() {
        let src_vs = nn::VarStore::new(Device::Cpu);
        let src_net = net::classifier(&src_vs.root());
        let slashed: Vec<(String, Tensor)> = src_vs
            .variables()
            .into_iter()
            .map(|(name, tensor)| (name.replace('.', "/"), tensor))
            .collect();
        let file = tempfile::Builder::new().suffix(".ot").tempfile().unwrap();
        Tensor::save_multi(&slashed, file.path()).unwrap();

        let loader = ModelLoader::new(file.path(), Device::Cpu);
        let loaded = loader.load_with_fallback();
        assert_eq!(loaded.strategy, LoadStrategy::Sanitized);

        let input = Tensor::rand([1, 3, 64, 64], (Kind::Float, Device::Cpu));
        let expected = tch::no_grad(|| src_net.forward_t(&input, false));
        let actual = loaded.net.forward(&input).unwrap();
        assert!(expected.allclose(&actual, 1e-5, 1e-8, false));
    }

    #[test]
    fn unrelated_weights_fall_through_to_the_untrained_fallback() {
        let artifact = write_artifact(&["some.other.net.weight"]);
        let loader = ModelLoader::new(artifact.path(), Device::Cpu);
        let loaded = loader.load_with_fallback();
        assert_eq!(loaded.strategy, LoadStrategy::FallbackUntrained);
    }

    #[test]
    fn loader_never_fails_on_missing_artifact() {
        let loader = ModelLoader::new("/nonexistent/model.ot", Device::Cpu);
        let loaded = loader.load_with_fallback();
        assert_eq!(loaded.strategy, LoadStrategy::FallbackUntrained);
        assert!(loaded.strategy.is_degraded());

        let input = Tensor::zeros([1, 3, 64, 64], (Kind::Float, Device::Cpu));
        let output = loaded.net.forward(&input).unwrap();
        assert_eq!(output.size(), vec![1, net::NUM_CLASSES]);
    }

    #[test]
    fn loader_never_fails_on_corrupt_artifact() {
        let file = tempfile::Builder::new().suffix(".ot").tempfile().unwrap();
        std::fs::write(file.path(), b"not a torch archive").unwrap();

        let loader = ModelLoader::new(file.path(), Device::Cpu);
        let loaded = loader.load_with_fallback();
        assert_eq!(loaded.strategy, LoadStrategy::FallbackUntrained);
    }
}
