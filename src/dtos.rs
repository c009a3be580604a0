pub mod labordtos;
pub mod walletdtos;
