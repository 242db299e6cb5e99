pub mod chatmodels;
pub mod documentmodel;
pub mod labourmodel;
pub mod usermodel;
