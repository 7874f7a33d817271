//! Interception core plugged into the proxy engine
//!
//! The engine owns the listener, TLS interception and upstream forwarding.
//! It takes its root signing identity from [`CertificateAuthority`] and runs
//! every exchange through a [`HookChain`].

pub mod body;
mod intercept;
mod tls;

pub use body::{BoxError, ProxyBody};
pub use intercept::{
    CaptureSettings, HookChain, Intercepted, RequestHook, ResponseHook, SessionRecorder,
    REQUEST_ID_HEADER,
};
pub use tls::{CertificateAuthority, CertificateInfo, RootIdentity, RootSubject, ROOT_KEY_BITS};
