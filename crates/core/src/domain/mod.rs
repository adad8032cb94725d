pub mod facts;
pub mod tool;
pub mod turn;
