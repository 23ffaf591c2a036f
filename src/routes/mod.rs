pub mod featured;
pub mod live;
