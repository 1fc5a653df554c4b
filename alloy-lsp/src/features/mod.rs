pub mod commands;
pub mod lenses;
pub mod panel;

#[cfg(test)]
pub(crate) mod test_support;
