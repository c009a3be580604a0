pub mod labour;
pub mod wallet;
