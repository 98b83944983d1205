pub mod status;

pub use status::{
    status_router, RunningStatusServer, StatusPublisher, StatusReport, StatusServer, WatchdogStatus,
};
