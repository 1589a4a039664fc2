pub mod eval;
pub mod ir;
pub mod matching;
