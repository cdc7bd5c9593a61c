pub mod rules;
pub mod run;
pub mod topology;
