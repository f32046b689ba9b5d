use std::io::{Read, Seek};

use super::*;

#[test]
fn test_env_value() {
    std::env::set_var("ZIMF_TEST_ENV_VALUE", "42");
    assert_eq!(env_value::<usize>("ZIMF_TEST_ENV_VALUE", 7), 42);
    std::env::set_var("ZIMF_TEST_ENV_VALUE", "not-a-number");
    assert_eq!(env_value::<usize>("ZIMF_TEST_ENV_VALUE", 7), 7);
    std::env::remove_var("ZIMF_TEST_ENV_VALUE");
    assert_eq!(env_value::<usize>("ZIMF_TEST_ENV_VALUE", 7), 7);
}

#[test]
fn test_file_helpers() -> Result<()> {
    let dir = std::env::temp_dir().join("zimf-util-test");
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("scratch.data");

    let mut fd = create_file_rw(file.as_os_str()).unwrap();
    write_file!(fd, b"hello world", &file, "writing scratch")?;

    let mut fd = open_file_r(file.as_os_str()).unwrap();
    let data = read_file!(fd, std::io::SeekFrom::Start(6), 5, "reading scratch")?;
    assert_eq!(&data, b"world");

    // create_file_rw truncates.
    let fd = create_file_rw(file.as_os_str()).unwrap();
    assert_eq!(fd.metadata().unwrap().len(), 0);

    Ok(())
}
