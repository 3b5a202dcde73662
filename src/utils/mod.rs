pub mod path;
pub mod sos;
pub mod string;
