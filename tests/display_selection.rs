mod common;

use common::TestEnv;

#[test]
fn test_unknown_screen_exits_before_placement() -> Result<(), Box<dyn std::error::Error>> {
    let mut env = TestEnv::new("unknown-screen");
    let log = env.log_path();

    env.start_compositor(&[
        "-l",
        log.to_str().ok_or("non UTF-8 path")?,
        "-s",
        "nonexistent",
        "--output",
        "HDMI-1:1920x1080+0+0",
    ])?;

    let status = env.wait_for_exit()?;
    assert_eq!(status.code(), Some(1));

    let contents = env.log();
    assert!(contents.contains("nonexistent"), "{contents}");
    assert!(contents.contains("HDMI-1 1920x1080+0+0"), "{contents}");
    assert!(!contents.contains("Placed "), "{contents}");
    assert!(!contents.contains("Headless compositor running"), "{contents}");
    Ok(())
}

#[test]
fn test_screen_names_match_case_insensitively() -> Result<(), Box<dyn std::error::Error>> {
    let mut env = TestEnv::new("screen-case");
    let log = env.log_path();

    env.start_compositor(&[
        "-l",
        log.to_str().ok_or("non UTF-8 path")?,
        "-s",
        "hdmi-2",
        "--output",
        "HDMI-1:1920x1080+0+0",
        "--output",
        "HDMI-2:1920x1080+1920+0",
        "--windows",
        "2",
    ])?;

    env.wait_for_log("runtime loop", |line| line.contains("Headless compositor running"))?;
    let contents = env.log();
    assert!(contents.contains("on HDMI-2 at 1920x1080+1920+0"), "{contents}");
    assert!(!contents.contains("on HDMI-1 "), "{contents}");
    assert_eq!(contents.matches("Placed ").count(), 1, "{contents}");

    let status = env.terminate()?;
    assert!(status.success(), "{status:?}");
    Ok(())
}
