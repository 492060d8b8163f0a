//! gRPC status <-> protocol error code mapping.

use agent_core::{ProtocolError, ProtocolErrorCode};
use tonic::{Code, Status};

pub fn status_to_protocol_error(status: &Status) -> ProtocolError {
    let code = match status.code() {
        Code::Unavailable => ProtocolErrorCode::ConnectionFailed,
        Code::DeadlineExceeded => ProtocolErrorCode::ConnectionTimeout,
        Code::Cancelled => ProtocolErrorCode::ConnectionClosed,
        Code::NotFound => ProtocolErrorCode::AgentNotFound,
        Code::InvalidArgument => ProtocolErrorCode::InvalidMessage,
        Code::FailedPrecondition => ProtocolErrorCode::AgentUnavailable,
        Code::Unimplemented => ProtocolErrorCode::UnsupportedVersion,
        _ => ProtocolErrorCode::ConnectionFailed,
    };
    ProtocolError::new(code, status.message().to_string())
}

pub fn protocol_error_to_status(error: &ProtocolError) -> Status {
    let code = match error.code {
        ProtocolErrorCode::ConnectionFailed => Code::Unavailable,
        ProtocolErrorCode::ConnectionTimeout => Code::DeadlineExceeded,
        ProtocolErrorCode::ConnectionClosed => Code::Cancelled,
        ProtocolErrorCode::AgentNotFound => Code::NotFound,
        ProtocolErrorCode::InvalidMessage | ProtocolErrorCode::MalformedPayload => Code::InvalidArgument,
        ProtocolErrorCode::AgentUnavailable | ProtocolErrorCode::CircuitOpen | ProtocolErrorCode::RateLimited => {
            Code::FailedPrecondition
        }
        ProtocolErrorCode::UnsupportedVersion => Code::Unimplemented,
        _ => Code::Internal,
    };
    Status::new(code, error.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_maps_to_connection_failed() {
        let status = Status::unavailable("down");
        let err = status_to_protocol_error(&status);
        assert_eq!(err.code, ProtocolErrorCode::ConnectionFailed);
    }

    #[test]
    fn deadline_exceeded_maps_to_connection_timeout() {
        let status = Status::deadline_exceeded("slow");
        let err = status_to_protocol_error(&status);
        assert_eq!(err.code, ProtocolErrorCode::ConnectionTimeout);
    }

    #[test]
    fn circuit_open_maps_to_failed_precondition() {
        let status = protocol_error_to_status(&ProtocolError::circuit_open("summarizer"));
        assert_eq!(status.code(), Code::FailedPrecondition);
    }
}
