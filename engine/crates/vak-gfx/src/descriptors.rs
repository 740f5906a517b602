pub mod bindless_table;
