pub mod staging_uploader;
