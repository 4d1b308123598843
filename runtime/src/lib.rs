// spicy-rt — runtime support for spicyc-generated parsers
//
// The pieces a compiled parser module and its host link against: the fiber
// runtime that lets parsers suspend on short input, monotonic byte streams,
// pack/unpack and incremental token matching primitives, the analyzer
// registry, and the runtime error taxonomy.

pub mod error;
pub mod fiber;
pub mod logging;
pub mod parser;
pub mod registry;
pub mod regexp;
pub mod stream;
pub mod unpack;
