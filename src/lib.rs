pub mod config;
pub mod logging;

use std::path::PathBuf;

use dimse::{DimseError, DimseScu, RemoteNode, Status};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;

/// How a run ended, mapped onto the process exit code
#[derive(Debug)]
pub enum Outcome {
    /// The peer stored the object (Success or Warning status)
    Stored(Status),
    /// The peer answered with a Failure, Cancel or Pending status
    Refused(Status),
    /// The input could not be prepared; nothing was sent
    Local(DimseError),
    /// No association was established; nothing was sent
    NotAssociated(DimseError),
    /// The association was established but the exchange did not complete
    Interrupted(DimseError),
}

impl Outcome {
    fn from_result(result: dimse::Result<Status>) -> Self {
        match result {
            Ok(status) if status.status.is_stored() => Outcome::Stored(status),
            Ok(status) => Outcome::Refused(status),
            Err(e) if e.is_local() => Outcome::Local(e),
            Err(e) if e.is_negotiation() => Outcome::NotAssociated(e),
            Err(e) => Outcome::Interrupted(e),
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            // Nothing was sent; the rejection or failure is only logged
            Outcome::Stored(_) | Outcome::NotAssociated(_) => 0,
            Outcome::Local(_) => 1,
            Outcome::Refused(_) | Outcome::Interrupted(_) => 2,
        }
    }
}

/// What to send and where
#[derive(Debug, Clone)]
pub struct Target {
    pub node: RemoteNode,
    pub file: PathBuf,
}

/// Store one file, logging the result the way the command line tool reports it
pub async fn run(config: Config, target: Target, cancel: CancellationToken) -> Outcome {
    debug!("$storescu v{} $", env!("CARGO_PKG_VERSION"));
    let scu = DimseScu::new(config.dimse);
    let outcome = Outcome::from_result(scu.store_file(&target.node, &target.file, &cancel).await);

    match &outcome {
        Outcome::Stored(status) if status.status.is_success() => {
            debug!("Store of {} completed: {}", target.file.display(), status)
        }
        Outcome::Stored(status) => warn!("Store of {} completed with warning: {}", target.file.display(), status),
        Outcome::Refused(status) => error!("Store of {} failed: {}", target.file.display(), status),
        Outcome::Local(e) => error!("{}", e),
        Outcome::NotAssociated(e) => error!(
            "Association with {}@{} not established: {}",
            target.node.ae_title,
            target.node.address(),
            e
        ),
        Outcome::Interrupted(DimseError::Cancelled) => warn!("Store of {} cancelled", target.file.display()),
        Outcome::Interrupted(e) => error!("Store of {} to {} failed: {}", target.file.display(), target.node.address(), e),
    }
    outcome
}
