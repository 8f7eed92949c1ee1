//! Spreadsheet adapters: calamine for reading source workbooks and
//! rust_xlsxwriter for exports.

pub mod excel_read;
pub mod excel_write;
