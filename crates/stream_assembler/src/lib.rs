//! Stream reassembly - turns raw incremental backend output into discrete,
//! displayable message chunks.

pub mod error;
pub mod policy;
pub mod reassembler;

pub use error::StreamFailure;
pub use policy::FlushPolicy;
pub use reassembler::{ReassemblerState, StreamReassembler};
