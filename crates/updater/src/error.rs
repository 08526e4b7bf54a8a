use thiserror::Error;

use crate::transport::TransportError;
use crate::units::ConversionError;

/// Conditions that end an update cycle early.
///
/// None of them is fatal for the process; the next tick starts from scratch.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("could not fetch stored rate of {asset}: {source}")]
    BaselineFetchFailed {
        asset: String,
        #[source]
        source: TransportError,
    },

    #[error("baseline read task failed: {0}")]
    BaselineTaskFailed(String),

    #[error("price for {asset} cannot be encoded: {source}")]
    Encode {
        asset: String,
        #[source]
        source: ConversionError,
    },

    #[error("rate update submission failed: {0}")]
    SubmissionFailed(#[source] TransportError),
}
