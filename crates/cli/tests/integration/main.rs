mod baseline_tests;
mod common;
mod deploy_tests;
mod manifest_tests;
mod update_tests;
