mod common;

mod fetch;
mod install;
