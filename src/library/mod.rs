pub mod library_manager;
