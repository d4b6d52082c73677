mod test_helpers;
mod pipeline_tests;
