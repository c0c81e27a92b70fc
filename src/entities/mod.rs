pub mod movie;
pub mod showtime;
pub mod theater;
