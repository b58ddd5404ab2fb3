//! Service-level lifecycle: handles, descriptor cache, scans, deletion.

use stackstore::{PixelFormat, StorageConfig, StorageError, StorageService};
use tempfile::TempDir;

use super::test_utils::{image_meta, plane};

fn service_with(capacity: usize, hard_limit: bool) -> StorageService {
    StorageService::new(StorageConfig {
        cache_capacity: capacity,
        cache_hard_limit: hard_limit,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn acquisition_loop_end_to_end() {
    let dir = TempDir::new().unwrap();
    let svc = service_with(8, false);

    // Create, configure axes, acquire, close - the driver's call sequence.
    let handle = svc
        .create(
            &dir.path().join("acq"),
            &[2, 3, 16, 16],
            PixelFormat::GRAY16,
            b"{\"experiment\":\"acq\"}",
        )
        .await
        .unwrap();

    for (axis, &(name, desc)) in [
        ("T", "Time point"),
        ("C", "Image channel"),
        ("Y", "Image height"),
        ("X", "Image width"),
    ]
    .iter()
    .enumerate()
    {
        svc.configure_dimension(&handle, axis, name, desc)
            .await
            .unwrap();
    }
    for c in 0..3usize {
        svc.configure_coordinate(&handle, 1, c, &format!("Channel{}", c))
            .await
            .unwrap();
    }

    for i in 0..6usize {
        let coord = [(i / 3) as u32, (i % 3) as u32];
        svc.add_image(
            &handle,
            &plane(PixelFormat::GRAY16, 16, 16, i as u8),
            Some(&coord),
            Some(&image_meta(i)),
        )
        .await
        .unwrap();
    }

    // Read-back during acquisition sees the committed bytes.
    let pixels = svc.get_image(&handle, Some(&[1, 2])).await.unwrap();
    assert!(pixels.iter().all(|&b| b == 5));

    svc.close(&handle).await.unwrap();

    // Reload through the service; the handle is the stored UUID.
    let path = svc.get_dataset_path(&handle).await.unwrap();
    let loaded = svc.load(&path).await.unwrap();
    assert_eq!(loaded, handle);

    assert_eq!(svc.get_shape(&loaded).await.unwrap(), vec![2, 3, 16, 16]);
    assert_eq!(
        svc.get_data_type(&loaded).await.unwrap(),
        PixelFormat::GRAY16
    );
    assert_eq!(svc.get_image_count(&loaded).await.unwrap(), 6);
    assert_eq!(
        &svc.get_summary_meta(&loaded).await.unwrap()[..],
        b"{\"experiment\":\"acq\"}"
    );

    let (name, desc) = svc.get_dimension(&loaded, 1).await.unwrap();
    assert_eq!((name.as_str(), desc.as_str()), ("C", "Image channel"));
    assert_eq!(
        svc.get_coordinate(&loaded, 1, 2).await.unwrap(),
        "Channel2"
    );

    for i in 0..6usize {
        let coord = [(i / 3) as u32, (i % 3) as u32];
        let pixels = svc.get_image(&loaded, Some(&coord)).await.unwrap();
        assert!(pixels.iter().all(|&b| b == i as u8));
        assert_eq!(
            svc.get_image_metadata(&loaded, Some(&coord)).await.unwrap(),
            image_meta(i)
        );
    }
}

#[tokio::test]
async fn list_scan_finds_exactly_the_datasets() {
    let dir = TempDir::new().unwrap();
    let svc = service_with(8, false);

    let a = svc
        .create(&dir.path().join("a"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();
    let b = svc
        .create(&dir.path().join("b"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();
    svc.close(&a).await.unwrap();
    svc.close(&b).await.unwrap();

    // Noise the scan must skip: a text file, a non-dataset directory, and
    // an empty .g2s directory without chunk files.
    std::fs::write(dir.path().join("c.txt"), b"noise").unwrap();
    std::fs::create_dir(dir.path().join("notes")).unwrap();
    std::fs::create_dir(dir.path().join("hollow.g2s")).unwrap();

    let found = svc.list(dir.path()).await.unwrap();
    assert_eq!(found.len(), 2);
    assert!(found[0].ends_with("a.g2s"));
    assert!(found[1].ends_with("b.g2s"));
}

#[tokio::test]
async fn sequential_service_reads() {
    let dir = TempDir::new().unwrap();
    let svc = service_with(8, false);
    let handle = svc
        .create(&dir.path().join("seq"), &[3, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();

    for i in 0..3usize {
        svc.add_image(
            &handle,
            &plane(PixelFormat::GRAY8, 8, 8, i as u8),
            None,
            Some(&image_meta(i)),
        )
        .await
        .unwrap();
    }
    svc.close(&handle).await.unwrap();
    let loaded = svc
        .load(&svc.get_dataset_path(&handle).await.unwrap())
        .await
        .unwrap();

    // Metadata at the cursor does not advance; image reads do.
    assert_eq!(
        svc.get_image_metadata(&loaded, None).await.unwrap(),
        image_meta(0)
    );
    for i in 0..3u8 {
        let pixels = svc.get_image(&loaded, None).await.unwrap();
        assert!(pixels.iter().all(|&b| b == i));
    }
    assert!(matches!(
        svc.get_image(&loaded, None).await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn eviction_respects_open_descriptors() {
    let dir = TempDir::new().unwrap();
    let svc = service_with(2, false);

    let a = svc
        .create(&dir.path().join("a"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();
    let b = svc
        .create(&dir.path().join("b"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();

    svc.close(&a).await.unwrap();

    // Admission at capacity evicts only the closed descriptor.
    let c = svc
        .create(&dir.path().join("c"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();

    assert!(matches!(
        svc.get_shape(&a).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(svc.get_shape(&b).await.is_ok());
    assert!(svc.get_shape(&c).await.is_ok());

    // The open dataset b still accepts appends after the churn.
    svc.add_image(&b, &plane(PixelFormat::GRAY8, 8, 8, 1), None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn hard_limit_fails_admission_when_all_open() {
    let dir = TempDir::new().unwrap();
    let svc = service_with(2, true);

    let _a = svc
        .create(&dir.path().join("a"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();
    let _b = svc
        .create(&dir.path().join("b"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();

    let result = svc
        .create(&dir.path().join("c"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await;
    assert!(matches!(result, Err(StorageError::OutOfResources(_))));
}

#[tokio::test]
async fn delete_closes_and_removes() {
    let dir = TempDir::new().unwrap();
    let svc = service_with(8, false);
    let handle = svc
        .create(&dir.path().join("gone"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();
    svc.add_image(&handle, &plane(PixelFormat::GRAY8, 8, 8, 1), None, None)
        .await
        .unwrap();

    let path = svc.get_dataset_path(&handle).await.unwrap();
    svc.delete(&handle).await.unwrap();

    assert!(!path.exists());
    assert!(matches!(
        svc.get_image(&handle, None).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(svc.list(dir.path()).await.unwrap().is_empty());
}

#[tokio::test]
async fn collision_suffix_reported_through_path() {
    let dir = TempDir::new().unwrap();
    let svc = service_with(8, false);

    let first = svc
        .create(&dir.path().join("dup"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();
    let second = svc
        .create(&dir.path().join("dup"), &[2, 8, 8], PixelFormat::GRAY8, b"")
        .await
        .unwrap();

    let first_path = svc.get_dataset_path(&first).await.unwrap();
    let second_path = svc.get_dataset_path(&second).await.unwrap();
    assert!(first_path.ends_with("dup.g2s"));
    assert!(second_path.ends_with("dup_1.g2s"));
}

#[tokio::test]
async fn concurrent_datasets_proceed_in_parallel() {
    let dir = TempDir::new().unwrap();
    let svc = std::sync::Arc::new(service_with(8, false));

    let mut handles = Vec::new();
    for name in ["p0", "p1", "p2"] {
        let handle = svc
            .create(&dir.path().join(name), &[4, 8, 8], PixelFormat::GRAY8, b"")
            .await
            .unwrap();
        handles.push(handle);
    }

    // Interleave appends to three datasets from three tasks.
    let mut tasks = Vec::new();
    for (t, handle) in handles.iter().cloned().enumerate() {
        let svc = svc.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..4u8 {
                svc.add_image(
                    &handle,
                    &plane(PixelFormat::GRAY8, 8, 8, t as u8 * 10 + i),
                    None,
                    None,
                )
                .await
                .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for (t, handle) in handles.iter().enumerate() {
        assert_eq!(svc.get_image_count(handle).await.unwrap(), 4);
        let pixels = svc.get_image(handle, Some(&[2])).await.unwrap();
        assert!(pixels.iter().all(|&b| b == t as u8 * 10 + 2));
    }
}
