//! Number classification service plus a four-instance client harness.
//!
//! The server classifies 32-bit integers sent by clients; the harness starts
//! four client instances whose startup order is constrained by a one-shot
//! gate and whose lifecycle is recorded in a shared liveness table.
//!
//! - [`cli`] parses the command line for server, client, and harness modes.
//! - [`protocol`] is the wire codec: 4-byte big-endian numbers up, text
//!   lines down, and the burst markers clients synchronise on.
//! - [`classify`] turns a number into its three response lines.
//! - [`server`] accepts TCP connections and serves each one on its own task.
//! - [`input`] reads operator input in a way that survives timed-out waits.
//! - [`session`] drives one interactive client session.
//! - [`client`] runs a standalone session from the terminal.
//! - [`liveness`] and [`gate`] hold the state shared between instances.
//! - [`harness`] runs the four instances and aggregates their final states.
//!
//! Unit tests sit next to each module; the `tests/` directory exercises the
//! server, the harness, and the compiled binary over real sockets.

pub mod classify;
pub mod cli;
pub mod client;
pub mod gate;
pub mod harness;
pub mod input;
pub mod liveness;
pub mod protocol;
pub mod server;
pub mod session;
