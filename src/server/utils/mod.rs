pub mod domain_utils;
