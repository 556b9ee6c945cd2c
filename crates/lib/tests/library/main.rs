mod common;
mod properties_tests;
mod release_flow_tests;
