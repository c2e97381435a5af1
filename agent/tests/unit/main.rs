mod test_certificate;
mod test_cleanup;
mod test_retry;
mod test_workflow;
