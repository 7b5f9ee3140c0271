use std::{sync::mpsc, thread, time::Duration};

use tfs::{Error, OpenFlags, TecnicoFs};

const POLL: Duration = Duration::from_millis(200);

#[test]
fn destroy_after_all_closed_waits_for_every_handle() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    let a = fs.open("/a", OpenFlags::CREATE)?;
    let b = fs.open("/b", OpenFlags::CREATE)?;

    let (done_tx, done_rx) = mpsc::channel();
    thread::scope(|s| {
        let fs = &fs;
        s.spawn(move || {
            fs.destroy_after_all_closed().unwrap();
            done_tx.send(()).unwrap();
        });

        // still blocked: two handles open, then one
        assert!(done_rx.recv_timeout(POLL).is_err());
        fs.close(a).unwrap();
        assert!(done_rx.recv_timeout(POLL).is_err());

        fs.close(b).unwrap();
        done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("destroy_after_all_closed should return once all handles close");
    });

    // the file system is gone until a fresh instance is created
    assert!(matches!(
        fs.open("/a", OpenFlags::empty()),
        Err(Error::Destroyed)
    ));
    assert!(matches!(fs.lookup("/a"), Err(Error::Destroyed)));
    Ok(())
}

#[test]
fn destroy_after_all_closed_returns_immediately_when_idle() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    fs.destroy_after_all_closed()?;
    assert!(matches!(
        fs.open("/x", OpenFlags::CREATE),
        Err(Error::Destroyed)
    ));
    Ok(())
}

#[test]
fn a_fresh_instance_starts_clean() -> anyhow::Result<()> {
    let fs = TecnicoFs::new()?;
    let h = fs.open("/persisting", OpenFlags::CREATE)?;
    fs.close(h)?;
    fs.destroy_after_all_closed()?;

    let fs = TecnicoFs::new()?;
    assert!(fs.lookup("/persisting").is_err());
    Ok(())
}
