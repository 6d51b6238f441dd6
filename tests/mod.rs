mod common;
mod desk_tests;
mod orchestrator_tests;
