use eyre::Result;

/// A trait for reading structured records. Modeled after the `Read` trait in the std.
pub trait ReadRecord {
    /// The type of the records that will be read.
    type Record;

    /// Read a single record from the input into the provided buffer.
    /// Returns `true` if a record was read and `false` if the end of the input was reached.
    fn read_record(&mut self, into: &mut Self::Record) -> Result<bool>;

    /// Fill a buffer with records from the input. Returns the number of records read, which could
    /// be less than the length of the buffer or equals 0 if the end of the input is reached.
    fn read_records(&mut self, into: &mut [Self::Record]) -> Result<usize> {
        let mut read = 0;
        for record in into.iter_mut() {
            if !self.read_record(record)? {
                break;
            }
            read += 1;
        }
        Ok(read)
    }

    /// Read all records from the input into the provided buffer.
    fn read_to_end(&mut self, into: &mut Vec<Self::Record>) -> Result<usize>
    where
        Self::Record: Default,
    {
        let mut read = 0;
        let mut record = Self::Record::default();
        while self.read_record(&mut record)? {
            into.push(std::mem::take(&mut record));
            read += 1;
        }
        Ok(read)
    }
}
