use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tb_core::{EnvironmentParameters, ReportSection, StepDetails, StepKind, TestExecutionState, TestStep};
use tracing::info;

use super::{ensure_kind, substitute_path, StepProcessor};
use crate::context::StepContext;
use crate::error::{Result, StepError};

/// Copies a file or a directory tree from the step's inputs to a destination.
pub struct FileCopyProcessor;

impl FileCopyProcessor {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

/// Recursively copy a directory tree. Returns the number of files copied.
async fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<usize> {
    tokio::fs::create_dir_all(dst).await?;
    let mut copied = 0;
    let mut entries = tokio::fs::read_dir(src).await?;
    while let Some(entry) = entries.next_entry().await? {
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if entry.file_type().await?.is_dir() {
            copied += Box::pin(copy_dir_recursive(&src_path, &dst_path)).await?;
        } else {
            tokio::fs::copy(&src_path, &dst_path).await?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// A file copied onto an existing directory lands inside it.
fn file_target(source: &Path, destination: &Path) -> PathBuf {
    match source.file_name() {
        Some(name) if destination.is_dir() => destination.join(name),
        _ => destination.to_path_buf(),
    }
}

#[async_trait]
impl StepProcessor for FileCopyProcessor {
    fn kind(&self) -> StepKind {
        StepKind::FileCopy
    }

    async fn process(
        &self,
        step: &TestStep,
        env: &EnvironmentParameters,
        ctx: &StepContext,
        section: &mut ReportSection,
    ) -> Result<TestExecutionState> {
        ensure_kind(self.kind(), step)?;
        let StepDetails::FileCopy {
            source,
            destination,
        } = &step.details
        else {
            return Err(StepError::VariantMismatch {
                processor: self.kind(),
                step: step.kind(),
            });
        };

        let source = ctx.resolve(step.order, &substitute_path(source, env));
        let destination = ctx.resolve(step.order, &substitute_path(destination, env));
        let metadata = match tokio::fs::metadata(&source).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StepError::MissingInput(source))
            }
            Err(e) => return Err(e.into()),
        };

        let copied = if metadata.is_dir() {
            copy_dir_recursive(&source, &destination).await?
        } else {
            let target = file_target(&source, &destination);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, &target).await?;
            1
        };

        info!(step = step.order, files = copied, destination = %destination.display(), "files copied");
        section.info(format!(
            "copied {copied} file(s) from {} to {}",
            source.display(),
            destination.display()
        ))?;
        Ok(TestExecutionState::Passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_tree_into_destination() {
        let scratch = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(scratch.path());
        let input = ctx.step_dir(1).join("payload");
        std::fs::create_dir_all(input.join("nested")).unwrap();
        std::fs::write(input.join("a.txt"), "a").unwrap();
        std::fs::write(input.join("nested").join("b.txt"), "b").unwrap();

        let mut env = EnvironmentParameters::new();
        env.insert("target".into(), target.path().display().to_string());
        let step = TestStep::new(
            1,
            StepDetails::FileCopy {
                source: "payload".into(),
                destination: "${target}/out".into(),
            },
        );
        let mut section = ReportSection::new(step.display_name());

        let state = FileCopyProcessor::new()
            .process(&step, &env, &ctx, &mut section)
            .await
            .unwrap();
        assert_eq!(state, TestExecutionState::Passed);
        assert_eq!(std::fs::read_to_string(target.path().join("out/a.txt")).unwrap(), "a");
        assert_eq!(
            std::fs::read_to_string(target.path().join("out/nested/b.txt")).unwrap(),
            "b"
        );
    }

    #[tokio::test]
    async fn missing_source_is_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(scratch.path());
        let step = TestStep::new(
            2,
            StepDetails::FileCopy {
                source: "absent".into(),
                destination: "out".into(),
            },
        );
        let mut section = ReportSection::new(step.display_name());
        let err = FileCopyProcessor::new()
            .process(&step, &EnvironmentParameters::new(), &ctx, &mut section)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::MissingInput(_)));
    }

    #[tokio::test]
    async fn wrong_variant_is_a_mismatch() {
        let ctx = StepContext::new(std::env::temp_dir());
        let step = TestStep::new(1, StepDetails::Console { executable: "true".into() });
        let mut section = ReportSection::new(step.display_name());
        let err = FileCopyProcessor::new()
            .process(&step, &EnvironmentParameters::new(), &ctx, &mut section)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::VariantMismatch {
                processor: StepKind::FileCopy,
                step: StepKind::Console
            }
        ));
    }
}
