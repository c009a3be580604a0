pub mod labourmodel;
pub mod usermodel;
pub mod walletmodels;
