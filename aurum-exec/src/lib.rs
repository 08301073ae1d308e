//! Order execution layer.
//!
//! `BrokerPort` is the seam between trading decisions and the terminal
//! connection: the bridge implements it over the live socket, the stub
//! implements it in memory for tests, and a file-based transport could
//! be swapped in behind the same trait. `OrderExecutor` adds the
//! retry discipline and ledger accounting around the raw commands.

pub mod error;
pub mod executor;
pub mod ports;
pub mod stub;

pub use error::{ExecError, ExecResult};
pub use executor::OrderExecutor;
pub use ports::{BrokerPort, OrderAck};
pub use stub::StubBroker;
