//! Domain types for the bar store

pub mod bar;
pub mod symbol;
pub mod timeframe;

pub use bar::Bar;
pub use symbol::{is_provider_safe_str, Symbol, SymbolError};
pub use timeframe::{Timeframe, TimeframeError, TimeframeUnit};
