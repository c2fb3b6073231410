mod embedded_storage;
