use tfs::{BLOCK_SIZE, OpenFlags, TecnicoFs};

#[test]
fn truncate_resets_the_file() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    let baseline = fs.free_block_count();

    let h = fs.open("/f1", OpenFlags::CREATE)?;
    assert_eq!(fs.write(h, &vec![7; 3 * BLOCK_SIZE])?, 3 * BLOCK_SIZE);
    fs.close(h)?;
    assert!(fs.free_block_count() < baseline);

    let h = fs.open("/f1", OpenFlags::TRUNC)?;
    let mut buf = [0; 64];
    assert_eq!(fs.read(h, &mut buf)?, 0);
    fs.close(h)?;

    // every block went back to the pool; the inode itself stays
    assert_eq!(fs.free_block_count(), baseline);
    assert!(fs.lookup("/f1").is_ok());
    Ok(())
}

#[test]
fn truncate_releases_the_indirect_region() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    let baseline = fs.free_block_count();

    // 12 blocks of data force two entries into the indirect block
    let h = fs.open("/f1", OpenFlags::CREATE)?;
    assert_eq!(fs.write(h, &vec![9; 12 * BLOCK_SIZE])?, 12 * BLOCK_SIZE);
    fs.close(h)?;
    // 12 data blocks plus the indirect block itself
    assert_eq!(fs.free_block_count(), baseline - 13);

    let h = fs.open("/f1", OpenFlags::TRUNC)?;
    fs.close(h)?;
    assert_eq!(fs.free_block_count(), baseline);

    // the freed blocks are reusable for other files
    for i in 0..12 {
        let path = format!("/reuse{i}");
        let h = fs.open(&path, OpenFlags::CREATE)?;
        assert_eq!(fs.write(h, &vec![1; BLOCK_SIZE])?, BLOCK_SIZE);
        fs.close(h)?;
    }
    Ok(())
}

#[test]
fn truncated_file_accepts_new_content() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;

    let h = fs.open("/f1", OpenFlags::CREATE)?;
    assert_eq!(fs.write(h, b"old content")?, 11);
    fs.close(h)?;

    let h = fs.open("/f1", OpenFlags::TRUNC)?;
    assert_eq!(fs.write(h, b"new")?, 3);
    fs.close(h)?;

    let h = fs.open("/f1", OpenFlags::empty())?;
    let mut buf = [0; 16];
    assert_eq!(fs.read(h, &mut buf)?, 3);
    assert_eq!(&buf[..3], b"new");
    fs.close(h)?;
    Ok(())
}
