//! `regscore-sourcer` -- the image sourcer plugin boundary.
//!
//! A sourcer is a separate process launched once at startup. The host
//! half ([`client::SourcerClient`]) spawns it, checks the handshake and
//! then exposes it as an [`ImageSource`](regscore_core::capability::ImageSource).
//! The plugin half ([`serve::serve_stdio`]) answers requests on
//! stdin/stdout for any [`serve::Sourcer`]. The wire format lives in
//! [`protocol`].
//!
//! [`roulette`] is the stock sourcer shipped as the
//! `regscore-sourcer-roulette` binary.

pub mod client;
pub mod protocol;
pub mod roulette;
pub mod serve;
