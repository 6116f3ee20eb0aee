// SPDX-License-Identifier: MIT

/*!
# ncalink

A client for the NCALayer signing service and the Electronic Digital
Signature (EDS) authentication flow built on top of it.

NCALayer is the local daemon that brokers access to a citizen's signing
credentials. It listens on a fixed loopback WebSocket endpoint and exposes
a small JSON request/response protocol: each request names a module and a
method, each response carries a status code and a payload. The protocol has
one awkward property this crate exists to tame: responses carry no request
identifier, so the only safe way to talk to the daemon is one call at a
time, in order.

## Components

The [`connection::ConnectionManager`] owns the single WebSocket to the
daemon: connecting is idempotent, closing is always safe, and interested
parties can watch the connection status. The [`correlate::Correlator`]
serializes calls on that connection and guarantees each settles exactly
once — with a response, a timeout, or a connection error. The
[`client::SigningClient`] wraps the daemon's operations in typed methods
and can probe whether the daemon is running at all.

On top of those, the [`auth::Authenticator`] runs the portal's login flow:
it has the daemon sign a freshly stamped challenge, sends the signature to
the portal backend for verification, and reconciles the returned identity
with the locally stored session — including the role precedence rules that
keep a profile refresh from downgrading a role established at login.

The portal backend and the session store are collaborators, not parts of
this crate: the backend is consumed through its REST contract
([`backend::BackendClient`]) and the store through the
[`session::SessionStore`] trait.

## Crate features

* **cli** -
  Include the `ncalink` diagnostic CLI for probing the daemon and
  inspecting credential stores. Disabled by default.
*/

pub mod auth;
pub mod backend;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlate;
pub mod error;
pub mod protocol;
pub mod session;
