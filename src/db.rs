pub mod db;
pub mod labourdb;
pub mod memorydb;
pub mod walletdb;
