use std::path::Path;

use ort::execution_providers::ExecutionProviderDispatch;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

/// How much of the machine an ONNX session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProfile {
    /// Default builder on the CPU provider.
    Cpu,
    /// Full graph optimisation, all cores for intra-op work and the
    /// platform accelerator when one exists.
    Accelerated,
}

/// Builds a session for `model_path`. Used both for the first load and when
/// a misbehaving model is reloaded from disk.
pub fn load_session(
    model_path: &Path,
    profile: SessionProfile,
) -> Result<Session, Box<dyn std::error::Error>> {
    let builder = Session::builder()?;
    let session = match profile {
        SessionProfile::Cpu => builder.commit_from_file(model_path)?,
        SessionProfile::Accelerated => {
            let intra_threads = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            builder
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_inter_threads(1)?
                .with_intra_threads(intra_threads)?
                .with_execution_providers(platform_providers())?
                .commit_from_file(model_path)?
        }
    };
    log::debug!("ONNX session ready: {} ({profile:?})", model_path.display());
    Ok(session)
}

/// CoreML on macOS, DirectML on Windows, nothing extra elsewhere. ort falls
/// back to CPU when a listed provider fails to register.
fn platform_providers() -> Vec<ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Vec::new()
    }
}
