use tfs::{BLOCK_SIZE, MAX_FILE_SIZE, MAX_OPEN_FILES, OpenFlags, TecnicoFs};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn small_write_then_read() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;

    let h = fs.open("/f1", OpenFlags::CREATE)?;
    assert_eq!(fs.write(h, b"hello")?, 5);
    fs.close(h)?;

    let h = fs.open("/f1", OpenFlags::empty())?;
    let mut buf = [0; 10];
    assert_eq!(fs.read(h, &mut buf)?, 5);
    assert_eq!(&buf[..5], b"hello");
    // the offset is at the end now
    assert_eq!(fs.read(h, &mut buf)?, 0);
    fs.close(h)?;
    Ok(())
}

#[test]
fn lookup_misses_unknown_names() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    assert!(fs.lookup("/nope").is_err());
    assert!(fs.open("/nope", OpenFlags::empty()).is_err());

    let h = fs.open("/yes", OpenFlags::CREATE)?;
    fs.close(h)?;
    assert!(fs.lookup("/yes").is_ok());
    assert!(fs.lookup("/nope").is_err());
    Ok(())
}

#[test]
fn rejects_malformed_paths() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    assert!(fs.open("", OpenFlags::CREATE).is_err());
    assert!(fs.open("/", OpenFlags::CREATE).is_err());
    assert!(fs.open("relative", OpenFlags::CREATE).is_err());
    Ok(())
}

#[test]
fn write_spanning_blocks() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    let data = pattern(3 * BLOCK_SIZE + 7);

    let h = fs.open("/span", OpenFlags::CREATE)?;
    assert_eq!(fs.write(h, &data)?, data.len());
    fs.close(h)?;

    let h = fs.open("/span", OpenFlags::empty())?;
    let mut buf = vec![0; data.len() + 32];
    assert_eq!(fs.read(h, &mut buf)?, data.len());
    assert_eq!(&buf[..data.len()], &data[..]);
    fs.close(h)?;
    Ok(())
}

#[test]
fn write_through_the_indirect_block() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    let data = pattern(11 * BLOCK_SIZE);

    let h = fs.open("/big", OpenFlags::CREATE)?;
    assert_eq!(fs.write(h, &data)?, data.len());
    fs.close(h)?;

    let h = fs.open("/big", OpenFlags::empty())?;
    let mut buf = vec![0; data.len()];
    assert_eq!(fs.read(h, &mut buf)?, data.len());
    assert_eq!(buf, data);
    fs.close(h)?;
    Ok(())
}

#[test]
fn write_clips_at_the_file_size_limit() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    let data = pattern(MAX_FILE_SIZE + 100);

    let h = fs.open("/limit", OpenFlags::CREATE)?;
    assert_eq!(fs.write(h, &data)?, MAX_FILE_SIZE);
    // the handle sits at the limit; nothing more fits
    assert_eq!(fs.write(h, b"x")?, 0);
    fs.close(h)?;

    let h = fs.open("/limit", OpenFlags::empty())?;
    let mut buf = vec![0; MAX_FILE_SIZE + 100];
    assert_eq!(fs.read(h, &mut buf)?, MAX_FILE_SIZE);
    assert_eq!(&buf[..MAX_FILE_SIZE], &data[..MAX_FILE_SIZE]);
    fs.close(h)?;
    Ok(())
}

#[test]
fn partial_overwrite_keeps_the_tail() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;

    let h = fs.open("/f1", OpenFlags::CREATE)?;
    assert_eq!(fs.write(h, b"0123456789")?, 10);
    fs.close(h)?;

    // overwriting the head must not shrink the file
    let h = fs.open("/f1", OpenFlags::empty())?;
    assert_eq!(fs.write(h, b"ab")?, 2);
    fs.close(h)?;

    let h = fs.open("/f1", OpenFlags::empty())?;
    let mut buf = [0; 16];
    assert_eq!(fs.read(h, &mut buf)?, 10);
    assert_eq!(&buf[..10], b"ab23456789");
    fs.close(h)?;
    Ok(())
}

#[test]
fn append_starts_at_the_end() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;

    let h = fs.open("/log", OpenFlags::CREATE)?;
    assert_eq!(fs.write(h, b"one")?, 3);
    fs.close(h)?;

    let h = fs.open("/log", OpenFlags::APPEND)?;
    assert_eq!(fs.write(h, b"two")?, 3);
    fs.close(h)?;

    let h = fs.open("/log", OpenFlags::empty())?;
    let mut buf = [0; 16];
    assert_eq!(fs.read(h, &mut buf)?, 6);
    assert_eq!(&buf[..6], b"onetwo");
    fs.close(h)?;
    Ok(())
}

#[test]
fn append_handles_target_end_of_file_at_write_time() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    let h = fs.open("/log", OpenFlags::CREATE)?;
    fs.close(h)?;

    // both handles are opened while the file is empty
    let h1 = fs.open("/log", OpenFlags::APPEND)?;
    let h2 = fs.open("/log", OpenFlags::APPEND)?;
    assert_eq!(fs.write(h1, b"aaaa")?, 4);
    assert_eq!(fs.write(h2, b"bb")?, 2);
    fs.close(h1)?;
    fs.close(h2)?;

    let h = fs.open("/log", OpenFlags::empty())?;
    let mut buf = [0; 16];
    assert_eq!(fs.read(h, &mut buf)?, 6);
    assert_eq!(&buf[..6], b"aaaabb");
    fs.close(h)?;
    Ok(())
}

#[test]
fn handle_slots_recycle() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    for _ in 0..3 * MAX_OPEN_FILES {
        let h = fs.open("/recycled", OpenFlags::CREATE)?;
        fs.close(h)?;
    }
    assert_eq!(fs.open_file_count(), 0);
    Ok(())
}

#[test]
fn closing_twice_fails() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    let h = fs.open("/f1", OpenFlags::CREATE)?;
    fs.close(h)?;
    assert!(fs.close(h).is_err());
    assert!(fs.read(h, &mut [0; 4]).is_err());
    assert!(fs.write(h, b"x").is_err());
    Ok(())
}
