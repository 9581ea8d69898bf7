#[cfg(test)]
mod flaky;
#[cfg(test)]
mod support;

#[cfg(test)]
mod breaker_tests;
#[cfg(test)]
mod sync_tests;
