pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Timed out: {message}")]
	Timeout { message: String },
	#[error("Request was cancelled.")]
	Cancelled,
	#[error("Stage {stage_id} failed: {message}")]
	StageFailed { stage_id: u32, message: String },
}
impl From<frameseek_providers::Error> for Error {
	fn from(err: frameseek_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
