// Known-answer vectors shared by the integration tests

pub mod kbkdf;
