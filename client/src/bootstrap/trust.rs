use std::fmt;

use crossbeam_channel::{Receiver, Sender};
use rustls::pki_types::CertificateDer;

/// A certificate that failed automatic validation, waiting for the consumer's decision.
///
/// Answer with [`accept`](Self::accept) or [`reject`](Self::reject). Dropping the request
/// without answering counts as a rejection.
pub struct TrustRequest {
    pub host: String,
    pub port: u16,
    /// DER encoded end-entity certificate the server presented
    pub certificate: CertificateDer<'static>,
    /// SHA-256 of `certificate`, colon separated hex, for display
    pub fingerprint: String,
    /// Why automatic validation failed, when it was attempted
    pub reason: Option<String>,
    pub responder: TrustResponder,
}

impl TrustRequest {
    pub fn accept(self) {
        self.responder.accept();
    }

    pub fn reject(self) {
        self.responder.reject();
    }
}

impl fmt::Debug for TrustRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("fingerprint", &self.fingerprint)
            .field("reason", &self.reason)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustDecision {
    Accept,
    Reject,
}

/// One-shot answer to a [`TrustRequest`]. Can be sent to another thread (e.g. a UI).
pub struct TrustResponder {
    decision: Sender<TrustDecision>,
}

impl TrustResponder {
    pub(crate) fn new() -> (Self, Receiver<TrustDecision>) {
        let (decision, receiver) = crossbeam_channel::bounded(1);
        (Self { decision }, receiver)
    }

    pub fn accept(self) {
        let _ = self.decision.send(TrustDecision::Accept);
    }

    pub fn reject(self) {
        let _ = self.decision.send(TrustDecision::Reject);
    }
}
