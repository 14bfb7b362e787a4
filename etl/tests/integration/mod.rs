mod filesystem_test;
mod isolation_test;
mod merge_test;
mod pipeline_test;
