/// Read access to the bucket holding pre-uploaded project source.
pub trait ProjectSourceStore {
    /// Every object key under `prefix`, in any order.
    fn list_object_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, String>;

    fn read_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String>;
}
