use std::sync::Arc;

use crate::cadence::{CadenceRules, CadenceTable};
use crate::outreach::dispatcher::DispatchSettings;
use crate::outreach::provider::Providers;

/// Everything besides the database that launches, sweeps and scheduling
/// depend on.
#[derive(Clone)]
pub struct Services {
    pub providers: Providers,
    pub cadence: Arc<dyn CadenceRules>,
    pub dispatch: DispatchSettings,
}

impl Services {
    pub fn new(providers: Providers, dispatch: DispatchSettings) -> Services {
        Services {
            providers,
            cadence: Arc::new(CadenceTable::default()),
            dispatch,
        }
    }

    pub fn with_cadence(mut self, cadence: Arc<dyn CadenceRules>) -> Services {
        self.cadence = cadence;
        self
    }
}
