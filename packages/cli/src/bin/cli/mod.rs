pub mod languages;
pub mod providers;
pub mod run;
