use docket::database::Docket;
use docket::errors::DocketResult;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Opens a fresh in-memory database for one test case, initializing
/// logging on first use.
pub fn create_test_db() -> DocketResult<Docket> {
    LOGGER.call_once(|| {
        colog::init();
    });
    Docket::open()
}
