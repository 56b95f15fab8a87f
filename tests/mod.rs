mod client_tests;
mod common;
mod gateway_tests;
