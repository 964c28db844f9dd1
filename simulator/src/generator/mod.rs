pub mod phantom;
pub mod pulse;
