pub mod photos {
    pub const COLUMNS: &str = r#"
           id
         , filename
         , deviceid
         , userid
         , width
         , height
         , latitude
         , longitude
         , accuracy
         , captured_at
         , description
         , tags
         , visible
         , rootid
         , isroot
         , animationfilename
    "#;

    pub const INSERT: &str = r#"
    INSERT INTO photo (
        filename
      , deviceid
      , userid
      , width
      , height
      , latitude
      , longitude
      , accuracy
      , captured_at
      , description
      , tags
      , rootid
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#;

    pub const SELECT_BY_ID: &str = r#"
    SELECT id
         , filename
         , deviceid
         , userid
         , width
         , height
         , latitude
         , longitude
         , accuracy
         , captured_at
         , description
         , tags
         , visible
         , rootid
         , isroot
         , animationfilename
      FROM photo
     WHERE id = ?
    "#;

    pub const UPDATE_DESCRIPTION: &str = r#"
    UPDATE photo
       SET description = ?
     WHERE id = ?
    "#;

    pub const UPDATE_TAGS: &str = r#"
    UPDATE photo
       SET tags = ?
     WHERE id = ?
    "#;

    pub const UPDATE_DIMENSIONS: &str = r#"
    UPDATE photo
       SET width = ?
         , height = ?
     WHERE id = ?
    "#;

    pub const HIDE: &str = r#"
    UPDATE photo
       SET visible = 0
         , isroot = 0
         , animationfilename = NULL
     WHERE id = ?
    "#;
}

pub mod chains {
    /// Visible members of a chain including its anchor, in frame order.
    pub const SELECT_MEMBERS: &str = r#"
    SELECT id
         , filename
         , deviceid
         , userid
         , width
         , height
         , latitude
         , longitude
         , accuracy
         , captured_at
         , description
         , tags
         , visible
         , rootid
         , isroot
         , animationfilename
      FROM photo
     WHERE (id = ? OR rootid = ?)
       AND visible = 1
     ORDER BY captured_at ASC, id ASC
    "#;

    /// Visible non-anchor members pointing at a root, in frame order.
    pub const SELECT_FOLLOWERS: &str = r#"
    SELECT id
         , filename
         , deviceid
         , userid
         , width
         , height
         , latitude
         , longitude
         , accuracy
         , captured_at
         , description
         , tags
         , visible
         , rootid
         , isroot
         , animationfilename
      FROM photo
     WHERE rootid = ?
       AND visible = 1
     ORDER BY captured_at ASC, id ASC
    "#;

    pub const MARK_ROOT: &str = r#"
    UPDATE photo
       SET isroot = 1
         , rootid = 0
     WHERE id = ?
    "#;

    pub const PROMOTE_ANCHOR: &str = r#"
    UPDATE photo
       SET rootid = 0
         , isroot = ?
         , animationfilename = NULL
     WHERE id = ?
    "#;

    pub const REPOINT_FOLLOWERS: &str = r#"
    UPDATE photo
       SET rootid = ?
     WHERE rootid = ?
       AND visible = 1
       AND id != ?
    "#;

    pub const COLLAPSE: &str = r#"
    UPDATE photo
       SET rootid = 0
         , isroot = 0
         , animationfilename = NULL
     WHERE id = ?
    "#;

    pub const SET_ANIMATION: &str = r#"
    UPDATE photo
       SET animationfilename = ?
     WHERE id = ?
       AND isroot = 1
       AND visible = 1
    "#;

    pub const SELECT_MISSING_ANIMATIONS: &str = r#"
    SELECT r.id
      FROM photo AS r
     WHERE r.isroot = 1
       AND r.visible = 1
       AND r.animationfilename IS NULL
       AND EXISTS (
           SELECT 1
             FROM photo AS m
            WHERE m.rootid = r.id
              AND m.visible = 1
       )
     ORDER BY r.id
    "#;
}

pub mod devices {
    pub const INSERT: &str = r#"
    INSERT INTO device (deviceip)
    VALUES (?)
    "#;

    pub const UPDATE_CREDENTIALS: &str = r#"
    UPDATE device
       SET deviceid = ?
         , devicehash = ?
     WHERE id = ?
    "#;

    pub const SELECT_BY_CREDENTIALS: &str = r#"
    SELECT id
         , deviceid
         , devicehash
         , userid
         , deviceip
      FROM device
     WHERE deviceid = ?
       AND devicehash = ?
    "#;

    pub const LINK_USER: &str = r#"
    UPDATE device
       SET userid = ?
     WHERE id = ?
    "#;

    pub const COUNT_FOR_USER: &str = r#"
    SELECT COUNT(*)
      FROM device
     WHERE userid = ?
    "#;
}

pub mod users {
    pub const INSERT: &str = r#"
    INSERT INTO photouser (
        email
      , validationcode
      , retrycount
    ) VALUES (?, ?, 0)
    ON CONFLICT (email) DO NOTHING
    "#;

    pub const SELECT_BY_EMAIL: &str = r#"
    SELECT id
         , email
         , hash
         , validationcode
         , retrycount
         , validated
         , allowmailing
         , displayname
      FROM photouser
     WHERE email = ?
    "#;

    pub const SELECT_BY_CREDENTIALS: &str = r#"
    SELECT id
         , email
         , hash
         , validationcode
         , retrycount
         , validated
         , allowmailing
         , displayname
      FROM photouser
     WHERE email = ?
       AND hash = ?
       AND hash != ''
    "#;

    pub const SELECT_BY_ID: &str = r#"
    SELECT id
         , email
         , hash
         , validationcode
         , retrycount
         , validated
         , allowmailing
         , displayname
      FROM photouser
     WHERE id = ?
    "#;

    pub const INCREMENT_RETRY: &str = r#"
    UPDATE photouser
       SET retrycount = retrycount + 1
     WHERE id = ?
    "#;

    pub const MARK_VALIDATED: &str = r#"
    UPDATE photouser
       SET retrycount = 0
         , validated = 1
         , hash = ?
     WHERE id = ?
    "#;

    pub const UPDATE_DISPLAY_NAME: &str = r#"
    UPDATE photouser
       SET displayname = ?
     WHERE id = ?
    "#;

    pub const UPDATE_ALLOW_MAILING: &str = r#"
    UPDATE photouser
       SET allowmailing = ?
     WHERE id = ?
    "#;
}

pub mod likes {
    pub const SELECT_VOTE: &str = r#"
    SELECT likes
      FROM likes
     WHERE rootid = ?
       AND userid = ?
    "#;

    pub const UPSERT: &str = r#"
    INSERT INTO likes (rootid, userid, likes)
    VALUES (?, ?, ?)
    ON CONFLICT (rootid, userid) DO UPDATE
       SET likes = excluded.likes
         , updated_at = datetime('now')
    "#;

    /// Carries a set's votes over to a new anchor. A non-zero vote already
    /// on the new anchor is replaced by the set's vote.
    pub const MOVE_TO_ROOT: &str = r#"
    INSERT INTO likes (rootid, userid, likes)
    SELECT ?, userid, likes
      FROM likes
     WHERE rootid = ?
       AND likes != 0
    ON CONFLICT (rootid, userid) DO UPDATE
       SET likes = excluded.likes
         , updated_at = datetime('now')
    "#;

    pub const DELETE_FOR_ROOT: &str = r#"
    DELETE FROM likes
     WHERE rootid = ?
    "#;

    pub const SELECT_TOTALS: &str = r#"
    SELECT likes
         , COUNT(*)
      FROM likes
     WHERE rootid = ?
       AND likes != 0
     GROUP BY likes
    "#;
}
