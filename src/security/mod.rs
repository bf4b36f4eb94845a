pub mod fs_policy;

#[cfg(test)]
mod fs_policy_tests;
