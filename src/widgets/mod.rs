pub mod controls;
pub mod datatable;
pub mod detail;
pub mod edit_form;
pub mod text_input;
