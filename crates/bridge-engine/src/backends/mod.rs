pub mod redis;

#[cfg(test)]
mod test_helpers;
