//! Broker transport error types shared by the router and the caller.

use thiserror::Error;

/// Errors raised by the message broker transport.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Could not connect to the broker.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stream or consumer setup failed.
    #[error("Setup error: {0}")]
    Setup(String),

    /// Publishing a message failed.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Subscribing to a reply destination failed.
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Receiving a message from a consumer failed.
    #[error("Receive error: {0}")]
    Receive(String),

    /// Acknowledging a delivery failed.
    #[error("Acknowledge error: {0}")]
    Acknowledge(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            BrokerError::Publish("no responders".to_string()).to_string(),
            "Publish error: no responders"
        );
        assert_eq!(
            BrokerError::Acknowledge("timeout".to_string()).to_string(),
            "Acknowledge error: timeout"
        );
    }
}
