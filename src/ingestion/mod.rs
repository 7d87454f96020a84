pub mod signal_parser;

pub use signal_parser::{normalize_symbol, parse_signal, ValidationError};
