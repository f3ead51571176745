use std::{collections::BTreeSet, path::Path};

use quantcal_core::bundle::load_bundle;
use quantcal_session::{SessionError, SessionLoader};

use super::{builder::InterpreterSessionBuilder, session::InterpreterSession};

/// Opens interpreter sessions on bundles written by `quantcal_core::bundle::save_bundle`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpreterSessionLoader {
    enable_profiling: bool,
}

impl InterpreterSessionLoader {
    pub const fn new() -> Self {
        Self {
            enable_profiling: false,
        }
    }

    pub const fn with_profiling_enabled(mut self, enable_profiling: bool) -> Self {
        self.enable_profiling = enable_profiling;
        self
    }
}

impl SessionLoader for InterpreterSessionLoader {
    type Session = InterpreterSession;

    fn load(
        &self,
        model_path: &Path,
        tags: &BTreeSet<String>,
    ) -> Result<InterpreterSession, SessionError> {
        let model = load_bundle(model_path)?;
        if &model.tags != tags {
            return Err(SessionError::TagsMismatch {
                requested: tags.clone(),
                found: model.tags,
            });
        }
        Ok(InterpreterSessionBuilder::new(model)
            .with_profiling_enabled(self.enable_profiling)
            .build())
    }
}
