pub mod advise;
pub mod cli;
pub mod run;
