//! Scheduled HTTP downlinks for ThingRelay.
//!
//! A downlink periodically calls an HTTP endpoint on behalf of a thing and
//! republishes the response as one of its messages.
//!
//! - [`model`] defines downlinks, schedules and time filters
//! - [`scheduler`] owns the per-downlink timers
//! - [`executor`] performs one rate-limited execution
//! - [`service`] manages stored downlinks

pub mod error;
pub mod executor;
pub mod limiter;
pub mod model;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod time_filter;
pub mod xml;

pub use error::DownlinkError;
pub use executor::{
    DownlinkExecutor, ExecutionSnapshot, ExecutionStats, HttpClient, HttpRequest, HttpResponse,
    ReqwestClient,
};
pub use limiter::HostRateLimiter;
pub use model::{Downlink, Frequency, Interval, Scheduler, TimeFilter, Trigger};
pub use repository::DownlinkRepository;
pub use scheduler::{DownlinkRunner, DownlinkScheduler};
pub use service::{DownlinkService, DownlinksBackup};
