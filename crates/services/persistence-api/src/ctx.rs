//! Service context

use persistence::PersistenceService;

/// The persistence API context, shared by all handlers.
#[derive(Clone)]
pub struct Ctx {
    pub service: PersistenceService,
}
